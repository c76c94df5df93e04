#![forbid(unsafe_code)]

//! Library behind the `export_shorts` batch binary: YouTube Data API
//! pipeline, CSV rendering and the storage backends the results land in.

pub mod config;
pub mod export;
pub mod gcp;
pub mod pipeline;
pub mod storage;
pub mod youtube;
