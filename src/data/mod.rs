pub mod attribute;
pub mod mapper;
pub mod resolver;
pub mod scope;
