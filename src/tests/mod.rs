// Cross-module tests
pub mod test_agent;
pub mod test_replay_buffer;
pub mod test_trainer;
