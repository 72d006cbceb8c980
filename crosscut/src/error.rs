// Copyright 2025 Crosscut Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Weaving error types

use thiserror::Error;

/// Result type for weaving operations
pub type WeaveResult<T> = Result<T, WeaveError>;

/// Errors that can occur while registering advice or calling a woven operation
#[derive(Debug, Error)]
pub enum WeaveError {
    /// Registration or dispatch targeted a name the owner does not define.
    /// Surfaced before any interception is installed.
    #[error("type `{owner}` has no operation named `{name}`")]
    OperationNotFound { owner: String, name: String },

    /// Dispatch received an instance whose type was never defined in the
    /// registry's method table.
    #[error("instance type has no operations defined in this registry")]
    OwnerNotFound,

    /// A typed operation or advice body was reached with the wrong concrete
    /// receiver. Unreachable through the public API; kept so downcasts stay
    /// total without panicking.
    #[error("operation dispatched with the wrong receiver, expected `{expected}`")]
    InstanceMismatch { expected: &'static str },

    /// An error raised by advice or by the original operation. Passed through
    /// verbatim to the caller of the woven operation, never wrapped.
    #[error(transparent)]
    Advice(#[from] anyhow::Error),
}
