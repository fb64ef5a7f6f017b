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

use super::pod::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Immutable, content-addressed snapshot of a stateful set's pod template.
///
/// `data` carries the captured template as canonical JSON; `revision` is the
/// monotonic sequence number assigned by the revision store. Two revisions
/// with equal `data` describe the same template regardless of name or number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ControllerRevision {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: Value,
    pub revision: i64,
}

impl ControllerRevision {
    pub fn new(metadata: ObjectMeta, data: Value, revision: i64) -> Self {
        Self {
            api_version: "apps.nanoset.io/v1".to_string(),
            kind: "ControllerRevision".to_string(),
            metadata,
            data,
            revision,
        }
    }

    /// Object name, or the empty string when unset.
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }
}
