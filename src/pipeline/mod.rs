pub mod document;
pub mod loader;
pub mod schedule;
pub mod song;

#[cfg(test)]
pub(crate) mod test_fixture;
