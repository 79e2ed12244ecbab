// Copyright 2025 StrongDM Inc
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use serde::Deserialize;

use crate::protocol::Opcode;

/// Captured request: opcode byte plus the hex of its payload.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    pub name: String,
    pub opcode: u8,
    pub payload_hex: String,
    #[allow(dead_code)]
    pub notes: Option<String>,
}

impl Fixture {
    pub fn opcode(&self) -> Opcode {
        Opcode::try_from(self.opcode)
            .unwrap_or_else(|err| panic!("fixture {} has a bad opcode: {err}", self.name))
    }

    pub fn payload(&self) -> Vec<u8> {
        hex::decode(&self.payload_hex)
            .unwrap_or_else(|err| panic!("fixture {} has bad payload hex: {err}", self.name))
    }
}

fn fixture_path(name: &str) -> PathBuf {
    [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures"]
        .iter()
        .collect::<PathBuf>()
        .join(name)
        .with_extension("json")
}

/// Loads `tests/fixtures/<name>.json`.
pub fn load_fixture(name: &str) -> Fixture {
    let path = fixture_path(name);
    let fixture: Fixture = std::fs::read_to_string(&path)
        .map_err(|err| err.to_string())
        .and_then(|data| serde_json::from_str(&data).map_err(|err| err.to_string()))
        .unwrap_or_else(|err| panic!("fixture {}: {err}", path.display()));
    assert_eq!(fixture.name, name, "fixture file and name disagree");
    fixture
}
