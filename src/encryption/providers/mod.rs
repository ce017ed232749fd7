#[cfg(feature = "aws")]
pub mod aws_kms;
pub mod local;

#[cfg(feature = "aws")]
pub use aws_kms::AwsKmsEncryptionProvider;
pub use local::LocalEncryptionProvider;
