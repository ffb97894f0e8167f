pub mod blast;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod domain;
pub mod entrez;
pub mod error;
pub mod fastq;
pub mod http;
pub mod normalize;
pub mod output;
pub mod pacing;
pub mod pairer;
pub mod pipeline;
pub mod workspace;
