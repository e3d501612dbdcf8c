pub mod cursor_store;
