pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod errors;
pub mod flow_config;
pub mod gate;
pub mod hooks;
pub mod init;
pub mod lane;
pub mod scheduler;
pub mod stage;
pub mod status;
pub mod tracker;
pub mod ui;
pub mod util;
