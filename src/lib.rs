pub mod cuts;
pub mod deadlock;
pub mod idl;
pub mod lbbd;
pub mod master;
pub mod parser;
pub mod problem;
pub mod solution;
pub mod solvers;
pub mod subproblem;

#[cfg(test)]
mod test_instances;
