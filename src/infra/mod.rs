// Adapters behind the application ports

pub mod http_client;
pub mod report_renderer;
