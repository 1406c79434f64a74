mod baseline_status;
mod convergence;
mod reset;
