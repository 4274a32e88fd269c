//! Minimal ROOT output: uncompressed files of `TH1D` shape templates.

pub mod file;
pub mod th1;
pub mod wbuffer;

pub use file::RootFileWriter;
pub use th1::Th1d;
