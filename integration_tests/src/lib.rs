//! Support code for the cancore integration tests: an object dictionary for
//! a small test node, and a mock CAN driver.

pub mod mock_can;
pub mod object_dict;
