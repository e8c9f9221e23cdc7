use super::DriverError;

/// One weight sensor under a foot.
#[allow(async_fn_in_trait)]
pub trait LoadCell {
    type Error: DriverError;

    async fn read(&mut self) -> Result<i32, Self::Error>;
}
