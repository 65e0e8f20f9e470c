mod intervals;
mod runs;
