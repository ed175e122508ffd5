pub mod accumulator;
pub mod codec;
pub mod corpus;
pub mod counting;
pub mod engine;
pub mod error;
pub mod fastq;
pub mod io;
pub mod model;
pub mod reduce;
pub mod stats;
