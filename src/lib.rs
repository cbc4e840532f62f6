// SPDX-License-Identifier: Apache-2.0

pub mod archive;
pub mod bounded_channel;
pub mod crypto;
pub mod discovery;
pub mod enrich;
pub mod forwarder;
pub mod init;
pub mod persistence;
pub mod pipeline;
pub mod position;
pub mod tail;
