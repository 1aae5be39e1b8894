pub mod network_tests;
pub mod notification_tests;
pub mod server_lifecycle_tests;
