//! Process entry points for Lattice: dedicated server, remote client and
//! singleplayer.

pub mod frame_loop;
pub mod modes;
pub mod paths;
pub mod session;
