pub type DocbenchResult<T> = anyhow::Result<T>;
