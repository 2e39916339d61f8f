mod tests_basic;
mod tests_edge_cases;
