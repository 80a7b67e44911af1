//! Problem encodings solved with the Benders driver, each with a monolithic
//! formulation to check the decomposition against.

pub mod dakota;
pub mod timetabling;
