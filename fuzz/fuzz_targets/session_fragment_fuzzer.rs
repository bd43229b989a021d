//! Fuzz target for session request reassembly
//!
//! Delivers a request through a scripted transport in arbitrary fragments,
//! with would-block pauses, interrupted reads and a trickling writer.
//!
//! # Invariants
//!
//! - The response equals `render_response` of the whole request
//! - The evaluator runs at most once
//! - Phases only move forward (Receiving, Responding, Closing)
//! - An empty request is closed without a response

#![no_main]

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
};

use arbitrary::Arbitrary;
use calcwire_core::{
    render_response, CloseReason, Phase, Session, SessionAction, SessionConfig,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Step {
    Data(Vec<u8>),
    WouldBlock,
    Interrupted,
}

#[derive(Debug, Arbitrary)]
struct Input {
    steps: Vec<Step>,
    chunk_size: u8,
    write_limits: Vec<u8>,
}

struct Script {
    steps: VecDeque<Step>,
}

impl Read for Script {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.steps.front_mut() {
            None => Ok(0),
            Some(Step::Data(bytes)) if bytes.is_empty() => {
                self.steps.pop_front();
                Err(io::ErrorKind::WouldBlock.into())
            },
            Some(Step::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                bytes.drain(..n);
                if bytes.is_empty() {
                    self.steps.pop_front();
                }
                Ok(n)
            },
            Some(Step::WouldBlock) => {
                self.steps.pop_front();
                Err(io::ErrorKind::WouldBlock.into())
            },
            Some(Step::Interrupted) => {
                self.steps.pop_front();
                Err(io::ErrorKind::Interrupted.into())
            },
        }
    }
}

struct Trickle {
    limits: VecDeque<u8>,
    written: Vec<u8>,
}

impl Write for Trickle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Exhausted limits accept everything so the session always drains.
        let limit = self.limits.pop_front().map_or(buf.len(), usize::from);
        if limit == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = limit.min(buf.len());
        self.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fuzz_target!(|input: Input| {
    let request: Vec<u8> = input
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::Data(bytes) => Some(bytes.as_slice()),
            _ => None,
        })
        .flatten()
        .copied()
        .collect();

    let config = SessionConfig {
        read_chunk_size: usize::from(input.chunk_size.max(1)),
        max_request_bytes: None,
    };
    let mut session = Session::new(config);
    let mut reader = Script { steps: input.steps.into() };

    let actions = loop {
        let actions = session.on_readable(&mut reader).unwrap();
        if !actions.is_empty() {
            break actions;
        }
        assert_eq!(session.phase(), Phase::Receiving);
    };

    if request.is_empty() {
        assert_eq!(actions, vec![SessionAction::Close { reason: CloseReason::EmptyRequest }]);
        assert_eq!(session.phase(), Phase::Closing);
        assert_eq!(session.evaluations(), 0);
        return;
    }

    assert_eq!(actions, vec![SessionAction::AwaitWritable]);
    assert_eq!(session.evaluations(), 1);
    assert!(session.on_readable(&mut reader).is_err());

    let mut writer = Trickle { limits: input.write_limits.into(), written: Vec::new() };
    let mut last = Vec::new();
    while session.phase() == Phase::Responding {
        last = session.on_writable(&mut writer).unwrap();
    }

    assert_eq!(last, vec![SessionAction::Close { reason: CloseReason::Completed }]);
    assert_eq!(writer.written, render_response(&request));
    assert_eq!(session.evaluations(), 1);
});
