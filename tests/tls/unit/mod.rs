mod test_bundle_parsing;
mod test_cipher_suites;
