pub mod no_tracer;
pub mod script;
pub mod stop;
pub mod struct_logger;
pub mod tracer;
