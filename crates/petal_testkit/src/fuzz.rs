//! Fuzz testing harnesses for PetalDB.
//!
//! This module provides fuzz targets that can be used with cargo-fuzz
//! or other fuzzing frameworks. Decoding targets must never panic;
//! the command target checks every result against the in-memory model.

use crate::fixtures::test_config;
use crate::generators::Command;
use crate::integration::ModelHarness;
use petal_core::{segment_file_name, DataType, Database, Entry, EntryHeader, FileId};
use std::fs;

/// Fuzz target for entry decoding.
///
/// Arbitrary bytes either decode to an entry that re-encodes to the same
/// bytes, or fail with an error.
pub fn fuzz_entry_decode(data: &[u8]) {
    if let Ok(entry) = Entry::decode(data) {
        let encoded = entry.encode();
        assert_eq!(&data[..encoded.len()], &encoded[..], "re-encoding mismatch");
    }
}

/// Fuzz target for header parsing.
pub fn fuzz_entry_header(data: &[u8]) {
    if let Ok(header) = EntryHeader::parse(data) {
        assert!(header.entry_size() >= Entry::HEADER_SIZE);
    }
    let _ = EntryHeader::is_end_marker(data);
}

/// Fuzz target for recovery: arbitrary bytes as the only string segment.
///
/// Opening must either succeed or fail with an error.
pub fn fuzz_segment_image(data: &[u8]) {
    let Ok(temp) = tempfile::tempdir() else {
        return;
    };
    let path = temp.path().join(segment_file_name(DataType::String, FileId::new(1)));
    if fs::write(path, data).is_err() {
        return;
    }
    if let Ok(db) = Database::open_with_config(temp.path(), test_config()) {
        let _ = db.key_count(DataType::String);
        let _ = db.close();
    }
}

/// Parses fuzzer input into commands over a small key space.
pub fn parse_commands(data: &[u8]) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut bytes = data.iter().copied();

    let key = |b: u8| format!("key-{}", b % 8).into_bytes();
    let member = |b: u8| format!("m{}", b % 6).into_bytes();

    while let (Some(op), Some(k), Some(arg)) = (bytes.next(), bytes.next(), bytes.next()) {
        let command = match op % 11 {
            0 => {
                let len = usize::from(arg % 32);
                let value: Vec<u8> = bytes.by_ref().take(len).collect();
                Command::Set { key: key(k), value }
            }
            1 => Command::Delete { key: key(k) },
            2 | 3 => Command::Push {
                key: key(k),
                value: vec![arg],
                right: op % 11 == 3,
            },
            4 => Command::Pop {
                key: key(k),
                right: arg % 2 == 1,
            },
            5 => Command::HSet {
                key: key(k),
                field: member(arg),
                value: vec![op, arg],
            },
            6 => Command::HDel {
                key: key(k),
                field: member(arg),
            },
            7 => Command::SAdd {
                key: key(k),
                member: member(arg),
            },
            8 => Command::SRem {
                key: key(k),
                member: member(arg),
            },
            9 => Command::ZAdd {
                key: key(k),
                score: f64::from(arg) - 128.0,
                member: member(op),
            },
            _ => Command::DeleteKey {
                key: key(k),
                data_type: DataType::ALL[usize::from(arg) % DataType::ALL.len()],
            },
        };
        commands.push(command);
    }

    commands
}

/// Fuzz target for database commands.
///
/// Runs the parsed commands against an in-memory database and the model,
/// panicking on the first disagreement.
pub fn fuzz_database_operations(data: &[u8]) {
    let commands = parse_commands(data);
    if commands.is_empty() {
        return;
    }
    let Ok(db) = Database::open_in_memory_with_config(test_config()) else {
        return;
    };
    let mut harness = ModelHarness::new(&db);
    harness.apply_all(&commands);
    harness.verify_all();
}
