mod tests_loading;
