mod admission;
mod config;
mod plugins;
mod runs;
mod tools;
