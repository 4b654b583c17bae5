// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use thiserror::Error;
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChartError {
    #[error("No plottable rows: none of {total} result rows had a numeric '{measure}' value")]
    NoPlottableRows { measure: String, total: usize },
    #[error("Chart specification is not data-serializable: {reason}")]
    NotSerializable { reason: String },
    #[error("Chart specification contains an executable value at '{path}'")]
    ExecutableValue { path: String },
    #[error("Invalid chart specification: {reason}")]
    InvalidSpec { reason: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KnowledgeError {
    #[error("Unknown chart type '{name}'")]
    UnknownChartType { name: String },
}

pub type Result<T> = std::result::Result<T, ChartError>;
