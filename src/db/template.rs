//! Template database operations

use async_trait::async_trait;
use uuid::Uuid;

use super::{PgStore, StoreError, TemplateStore};
use crate::pagination::PageRequest;
use crate::template::model::Template;

const TEMPLATE_COLUMNS: &str = "id, user_id, name, description, content, created_at, updated_at";

#[async_trait]
impl TemplateStore for PgStore {
    async fn insert_template(&self, template: &Template) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO templates (id, user_id, name, description, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(template.id)
        .bind(template.user_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.content)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid, user_id: Uuid) -> Result<Option<Template>, StoreError> {
        let query = format!(
            "SELECT {} FROM templates WHERE id = $1 AND user_id = $2",
            TEMPLATE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Template>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_templates(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<(Vec<Template>, i64), StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM templates WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let query = format!(
            "SELECT {} FROM templates WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            TEMPLATE_COLUMNS
        );
        let items = sqlx::query_as::<_, Template>(&query)
            .bind(user_id)
            .bind(page.limit())
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;

        Ok((items, total))
    }

    async fn update_template(&self, template: &Template) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE templates
            SET name = $3, description = $4, content = $5, updated_at = $6
            WHERE id = $1 AND user_id = $2
            "#,
        )
        .bind(template.id)
        .bind(template.user_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.content)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_template_cascade(
        &self,
        id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Vec<String>>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes against in-flight batch commits holding FOR SHARE.
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM templates WHERE id = $1 AND user_id = $2 FOR UPDATE")
                .bind(id)
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let paths: Vec<String> = sqlx::query_scalar(
            "DELETE FROM documents WHERE template_id = $1 RETURNING storage_path",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM templates WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(paths))
    }
}
