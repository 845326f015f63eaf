// Config module - 配置加载与校验

pub mod loader;
pub mod model;
