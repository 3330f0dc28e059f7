pub mod context;
pub mod entities;
pub mod evaluator;
pub mod gate;
pub mod grammar;
pub mod lexer;
pub mod locale;
pub mod parser;
pub mod pipeline;
pub mod transforms;
