mod engine;
mod legalize;
