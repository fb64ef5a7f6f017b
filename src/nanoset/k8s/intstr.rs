/*
 * Copyright (C) 2024 The Nanocloud Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Value that is either an absolute count or a percentage of a total,
/// mirroring the cluster API's `maxUnavailable`-style fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(untagged)]
pub enum IntOrString {
    Int(i32),
    String(String),
}

impl IntOrString {
    /// Resolves the value against `total`. Percentages round down unless
    /// `round_up` is set.
    pub fn resolve(&self, total: i32, round_up: bool) -> Result<i32, IntOrStringError> {
        match self {
            IntOrString::Int(value) => Ok(*value),
            IntOrString::String(raw) => {
                let digits = raw
                    .strip_suffix('%')
                    .ok_or_else(|| IntOrStringError::Malformed(raw.clone()))?;
                let percent: i64 = digits
                    .trim()
                    .parse()
                    .map_err(|_| IntOrStringError::Malformed(raw.clone()))?;
                if percent < 0 {
                    return Err(IntOrStringError::Malformed(raw.clone()));
                }
                let scaled = percent * i64::from(total);
                let value = if round_up {
                    (scaled + 99) / 100
                } else {
                    scaled / 100
                };
                Ok(value as i32)
            }
        }
    }
}

impl Display for IntOrString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IntOrString::Int(value) => write!(f, "{}", value),
            IntOrString::String(raw) => f.write_str(raw),
        }
    }
}

/// Errors raised while resolving an [`IntOrString`].
#[derive(Debug)]
pub enum IntOrStringError {
    Malformed(String),
}

impl Display for IntOrStringError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IntOrStringError::Malformed(raw) => {
                write!(f, "invalid percentage value {:?}", raw)
            }
        }
    }
}

impl Error for IntOrStringError {}
