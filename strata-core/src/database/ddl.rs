use strata_model::{ColumnType, TableSchema};

use super::sql::{quote_ident, quote_literal, quote_qualified, quoted_list};

/// Statements that idempotently create `schema`'s table, its primary key,
/// its indexes and its column comments. Meant to run in one transaction.
pub fn create_table_statements(schema: &TableSchema) -> Vec<String> {
    let table = quote_qualified(&schema.name);

    let mut columns: Vec<String> = schema
        .columns
        .iter()
        .map(|col| {
            let mut def = format!("{} {}", quote_ident(&col.name), col.column_type);
            if let Some(constraints) =
                col.constraints.as_deref().filter(|c| !c.trim().is_empty())
            {
                def.push(' ');
                def.push_str(constraints.trim());
            }
            def
        })
        .collect();

    if let Some(ts) = schema.timestamp_column()
        && schema.column(ts).is_none()
    {
        columns.push(format!(
            "{} {} DEFAULT CURRENT_TIMESTAMP",
            quote_ident(ts),
            ColumnType::Timestamp
        ));
    }

    if !schema.primary_keys.is_empty() {
        columns.push(format!(
            "PRIMARY KEY ({})",
            quoted_list(&schema.primary_keys)
        ));
    }

    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {}\n)",
        columns.join(",\n    ")
    )];

    for index in &schema.indexes {
        statements.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {table} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&index.resolved_name(&schema.name)),
            quoted_list(&index.columns),
        ));
    }

    for col in &schema.columns {
        if let Some(comment) = col.comment.as_deref() {
            statements.push(format!(
                "COMMENT ON COLUMN {table}.{} IS {}",
                quote_ident(&col.name),
                quote_literal(comment)
            ));
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_model::{ColumnDef, IndexSpec};

    fn daily() -> TableSchema {
        TableSchema::new(
            "market.daily",
            vec![
                ColumnDef::new("ts_code", ColumnType::Varchar(16))
                    .with_constraints("NOT NULL"),
                ColumnDef::new("trade_date", ColumnType::Date)
                    .with_comment("trading day"),
                ColumnDef::new(
                    "close",
                    ColumnType::Numeric {
                        precision: 15,
                        scale: 4,
                    },
                ),
            ],
        )
        .with_primary_keys(["ts_code", "trade_date"])
        .with_date_column("trade_date")
        .with_index(IndexSpec {
            name: None,
            columns: vec!["trade_date".into()],
            unique: false,
        })
    }

    #[test]
    fn emits_table_index_and_comment() {
        let stmts = create_table_statements(&daily());
        assert_eq!(stmts.len(), 3);
        assert!(stmts[0].starts_with(r#"CREATE TABLE IF NOT EXISTS "market"."daily""#));
        assert!(stmts[0].contains(r#""ts_code" VARCHAR(16) NOT NULL"#));
        assert!(stmts[0].contains(r#""update_time" TIMESTAMP DEFAULT CURRENT_TIMESTAMP"#));
        assert!(stmts[0].contains(r#"PRIMARY KEY ("ts_code", "trade_date")"#));
        assert_eq!(
            stmts[1],
            r#"CREATE INDEX IF NOT EXISTS "idx_daily_trade_date" ON "market"."daily" ("trade_date")"#
        );
        assert_eq!(
            stmts[2],
            r#"COMMENT ON COLUMN "market"."daily"."trade_date" IS 'trading day'"#
        );
    }

    #[test]
    fn declared_timestamp_column_is_not_duplicated() {
        let mut schema = daily();
        schema
            .columns
            .push(ColumnDef::new("update_time", ColumnType::TimestampTz));
        let stmts = create_table_statements(&schema);
        assert_eq!(stmts[0].matches("update_time").count(), 1);

        let stmts = create_table_statements(&daily().without_timestamp());
        assert!(!stmts[0].contains("update_time"));
    }
}
