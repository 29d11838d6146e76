pub mod call;
pub mod mock_cmd;
