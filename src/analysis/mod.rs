pub mod lockcheck;
