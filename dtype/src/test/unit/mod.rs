mod cast;
mod dtype;
