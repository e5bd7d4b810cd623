pub mod dump;
pub mod options;
pub mod rsp;
pub mod target;
