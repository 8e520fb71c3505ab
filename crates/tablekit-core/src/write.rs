//! Write terminals of [`Query`]: create, upsert, field updates and deletes.

use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::expr::{Compiler, VersionCheck};
use crate::item::{
    Stamp, field_updates, key_from_conditions, prepare_item, record_json, record_key,
    record_version,
};
use crate::query::Query;
use crate::schema::Record;
use crate::update::{UpdateBuilder, UpdateSpec};

impl<'c, T: Record> Query<'c, T> {
    /// Put a new record. Stamps both timestamps and initializes the version
    /// to 0. With [`if_not_exists`](Self::if_not_exists) the put fails when
    /// the key is taken.
    #[instrument(skip_all, fields(table = %self.table(), operation = "create"))]
    pub async fn create(mut self, record: &T) -> Result<()> {
        let schema = self.prepare()?;
        let codec = self.client.codec();
        let item = prepare_item(&schema, codec, record, Stamp::Create)?;

        let mut compiler = Compiler::new(&schema, codec);
        if self.if_not_exists {
            compiler.key_exists(false)?;
        }
        self.apply_conditions(&mut compiler)?;
        let request = compiler.finish()?;

        debug!(
            guarded = request.condition.is_some(),
            "creating item"
        );
        let input = request.into_put_input(item);
        self.client
            .send(&self.token, || self.client.transport().put_item(input.clone()))
            .await?;
        Ok(())
    }

    /// Put a record, replacing whatever is stored. Keeps a `created_at` the
    /// record already carries. Never adds an existence guard.
    #[instrument(skip_all, fields(table = %self.table(), operation = "create_or_update"))]
    pub async fn create_or_update(mut self, record: &T) -> Result<()> {
        let schema = self.prepare()?;
        let codec = self.client.codec();
        let item = prepare_item(&schema, codec, record, Stamp::Upsert)?;

        let mut compiler = Compiler::new(&schema, codec);
        self.apply_conditions(&mut compiler)?;
        let request = compiler.finish()?;

        let input = request.into_put_input(item);
        self.client
            .send(&self.token, || self.client.transport().put_item(input.clone()))
            .await?;
        Ok(())
    }

    /// Copy `fields` from `record` onto the stored item. Versioned records are
    /// guarded by the version they carry and the stored version is bumped.
    #[instrument(skip_all, fields(table = %self.table(), operation = "update_fields"))]
    pub async fn update_fields(mut self, record: &T, fields: &[&str]) -> Result<()> {
        if fields.is_empty() {
            return Err(Error::validation("update_fields needs at least one field"));
        }
        let schema = self.prepare()?;
        let json = record_json(record)?;
        let key = record_key(&schema, self.client.codec(), &json)?;
        let spec = UpdateSpec::from_ops(field_updates(&schema, &json, fields)?);
        let known = record_version(&schema, &json);
        self.run_update(&schema, key, spec, None, known).await?;
        Ok(())
    }

    /// Start a fine-grained update of the item named by the `where` clauses.
    #[must_use]
    pub fn update_builder(self) -> UpdateBuilder<'c, T> {
        UpdateBuilder::new(self)
    }

    /// Delete the item named by the `where` clauses.
    #[instrument(skip_all, fields(table = %self.table(), operation = "delete"))]
    pub async fn delete(mut self) -> Result<()> {
        let schema = self.prepare()?;
        let codec = self.client.codec();
        let key = key_from_conditions(&schema, codec, &self.conditions)?.ok_or_else(|| {
            Error::validation("delete needs an equality condition on every key attribute")
        })?;

        let mut compiler = Compiler::new(&schema, codec);
        self.apply_conditions(&mut compiler)?;
        let request = compiler.finish()?;
        let input = request.into_delete_input(key);
        self.client
            .send(&self.token, || self.client.transport().delete_item(input.clone()))
            .await?;
        Ok(())
    }

    /// Delete a record by its key, guarded by its version when it has one.
    #[instrument(skip_all, fields(table = %self.table(), operation = "delete_record"))]
    pub async fn delete_record(mut self, record: &T) -> Result<()> {
        let schema = self.prepare()?;
        let codec = self.client.codec();
        let json = record_json(record)?;
        let key = record_key(&schema, codec, &json)?;

        let mut compiler = Compiler::new(&schema, codec);
        let caller_guarded = schema
            .version_attribute()
            .is_some_and(|a| compiler.references_attribute(&self.write_conditions, a));
        if let Some(version) = record_version(&schema, &json).filter(|v| *v != 0)
            && !caller_guarded
        {
            compiler.version_condition(VersionCheck::Equals(version))?;
        }
        self.apply_conditions(&mut compiler)?;
        let request = compiler.finish()?;
        let input = request.into_delete_input(key);
        self.client
            .send(&self.token, || self.client.transport().delete_item(input.clone()))
            .await?;
        Ok(())
    }
}
