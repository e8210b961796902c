#![allow(unused_imports)]

pub use block_loader::testing::{
    build_file, expected_output, make_header, payload, KeystreamOracle,
};
