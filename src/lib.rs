pub mod commands;
pub mod dpt9001;
pub mod facade;
pub mod http;
pub mod modbus;
pub mod output;
pub mod registers;
pub mod server;
pub mod slave;
pub mod store;
