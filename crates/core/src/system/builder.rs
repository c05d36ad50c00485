// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::Machine;
use halley_config::BoardDescriptor;
use std::path::Path;
use tracing::info;

/// Builds a machine from a board descriptor path.
/// If no path is provided, the built-in Halley6 map is used.
pub fn build_machine(board_path: Option<&Path>) -> anyhow::Result<Machine> {
    let board = if let Some(path) = board_path {
        info!("Loading board descriptor: {:?}", path);
        BoardDescriptor::from_file(path)?
    } else {
        info!("Using built-in Halley6 board");
        BoardDescriptor::halley6()
    };

    super::halley6::build(&board)
}
