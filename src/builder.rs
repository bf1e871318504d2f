use crate::{DatabaseHandle, Encoding, Environment, HandleError, NativeGateway, OpenFlags, Transaction};

/// Builder for opening a [`DatabaseHandle`] in an environment.
///
/// Anything left unset falls back to the environment's configuration.
pub struct DatabaseOpenOptions<'env, G: NativeGateway> {
    env: &'env Environment<G>,
    name: Option<String>,
    flags: Option<OpenFlags>,
    encoding: Option<Encoding>,
}

impl<'env, G: NativeGateway> DatabaseOpenOptions<'env, G> {
    pub fn new(env: &'env Environment<G>) -> Self {
        Self {
            env,
            name: None,
            flags: None,
            encoding: None,
        }
    }

    /// Set the database name. Without one the main database is opened.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    /// Open the database with the given transaction
    pub fn open<T>(self, txn: &mut T) -> Result<DatabaseHandle<G>, HandleError>
    where
        T: Transaction<Gateway = G>,
    {
        DatabaseHandle::open(
            self.env,
            txn,
            self.name.as_deref(),
            self.flags,
            self.encoding,
        )
    }
}
