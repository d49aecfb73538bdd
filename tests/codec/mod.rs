//! Frame codec and header compression tests

mod frame_parsing;
