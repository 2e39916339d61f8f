mod tests_framing;
