/*
BSD 2-Clause License

Copyright (c) 2022, Diagnosis and Control of Clouds Laboratory
All rights reserved.

Redistribution and use in source and binary forms, with or without
modification, are permitted provided that the following conditions are met:

1. Redistributions of source code must retain the above copyright notice, this
   list of conditions and the following disclaimer.

2. Redistributions in binary form must reproduce the above copyright notice,
   this list of conditions and the following disclaimer in the documentation
   and/or other materials provided with the distribution.

THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS"
AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE
FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER
CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY,
OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
*/

use thiserror::Error;

/// The error kinds shared across the coordinator, node agent and peer-sync
/// server. Every fallible operation in the fabric returns one of these.
#[derive(Error, Debug)]
pub enum QotError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("coordination session lost")]
    SessionLost,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("peer-sync topology error: {0}")]
    TopologyError(String),

    #[error("translation error: {0}")]
    TranslationError(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

pub type QotResult<T> = Result<T, QotError>;

/// Binding-API boundary return codes (§7): the only error surface a client
/// application ever observes, everything else is collapsed into one of
/// these three codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReturnCode {
    Ok = 0,
    Err = 1,
    ConnErr = 2,
}

impl From<&QotError> for ReturnCode {
    fn from(e: &QotError) -> ReturnCode {
        match e {
            QotError::ConnectionError(_) | QotError::SessionLost => ReturnCode::ConnErr,
            _ => ReturnCode::Err,
        }
    }
}

impl From<ReturnCode> for i32 {
    fn from(r: ReturnCode) -> i32 {
        r as i32
    }
}

impl TryFrom<i32> for ReturnCode {
    type Error = QotError;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ReturnCode::Ok),
            1 => Ok(ReturnCode::Err),
            2 => Ok(ReturnCode::ConnErr),
            other => Err(QotError::InvalidArgument(format!("unknown retval {other}"))),
        }
    }
}

impl serde::Serialize for ReturnCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i32(*self as i32)
    }
}

impl<'de> serde::Deserialize<'de> for ReturnCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = i32::deserialize(deserializer)?;
        ReturnCode::try_from(v).map_err(serde::de::Error::custom)
    }
}
