// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::fmt::{Display, Formatter};

const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_GIT_REVISION: Option<&str> = option_env!("NETD_BUILD_GIT_REVISION");
const BUILD_STATUS: Option<&str> = option_env!("NETD_BUILD_STATUS");

#[derive(Clone, Debug, Default)]
pub struct BuildInfo {
    version: String,
    git_revision: String,
    build_status: String,
}

impl BuildInfo {
    pub fn new() -> Self {
        BuildInfo {
            version: BUILD_VERSION.to_string(),
            git_revision: BUILD_GIT_REVISION.unwrap_or("unknown").to_string(),
            build_status: BUILD_STATUS.unwrap_or("unknown").to_string(),
        }
    }
}

impl Display for BuildInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "netd {} (revision {}, {})",
            self.version, self.git_revision, self.build_status
        )
    }
}
