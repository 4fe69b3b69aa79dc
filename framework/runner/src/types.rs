/// Recommended error type for your scenario `main` function. Errors from building or running a
/// scenario convert into it, so you can use `?` to propagate them.
pub type StampedeResult<T> = anyhow::Result<T>;
