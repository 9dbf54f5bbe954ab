/*!
 * Transfer core: planning, parallel data movement, and replica bookkeeping
 */

pub mod checksum;
pub mod circular_buffer;
pub mod engine;
pub mod glacier;
pub mod naming;
pub mod planner;
pub mod reader;
pub mod replica;
pub mod retry;
