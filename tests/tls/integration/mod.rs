mod test_file_identity;
mod test_secure_listener;
