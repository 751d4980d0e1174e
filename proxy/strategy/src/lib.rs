// Copyright 2022 SphereEx Authors
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

pub mod config;
pub mod datanode;
pub mod inline;
pub mod keygen;
pub mod readwritesplitting;
pub mod result;
pub mod route;
pub mod rule;
pub mod schema;
pub mod sharding;
pub mod sharding_rewrite;
pub mod sharding_route;
pub mod stmt;
pub mod value;

pub use route::{Route, RouteHints, RouteInput};
