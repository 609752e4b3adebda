// Copyright (c) 2026 Forge Authors
// SPDX-License-Identifier: Apache-2.0

pub mod job;
pub mod sampler;
pub mod worker;
