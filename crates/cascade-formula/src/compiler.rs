//! Lowering a formula template to one executable refresh statement.
//!
//! The emitted statement is self-contained: it reads the staged root ids
//! from `tmp_dynamiccolumn_ids`, computes the formula per root row through a
//! chain of per-related-table CTEs, and updates only rows whose value
//! actually changed (`IS DISTINCT FROM`).

use std::collections::{BTreeMap, BTreeSet};

use cascade_core::column::{ColumnDependency, DependencyMap};
use cascade_core::model::{ID_COLUMN, IS_DELETED_COLUMN, ModelsMap, STAGING_IDS_TABLE};
use cascade_relation::graph::{RelationGraph, RelationLink};
use cascade_relation::join::{hop_columns, inverse_join_chain, left_join_chain};

use crate::parser::{
    normalize_sql, parse_variables, replace_bare_ident, rewrite_table_refs, scan_table_refs,
};
use crate::types::{CompiledFormula, FormulaCte, FormulaError, Variable};

/// Compiles `(root, column, formula, variables)` into the refresh statement
/// and its derived dependency map.
pub fn compile(
    models: &ModelsMap,
    graph: &RelationGraph,
    root: &str,
    column: &str,
    formula_text: &str,
    variables_text: &str,
) -> Result<CompiledFormula, FormulaError> {
    let variables = parse_variables(variables_text)?;
    let formula = normalize_sql(formula_text);

    for reference in scan_table_refs(&formula) {
        ensure_known_table(models, &reference.table)?;
    }
    for var in &variables {
        ensure_known_table(models, &var.table)?;
        for reference in scan_table_refs(&var.expr) {
            ensure_known_table(models, &reference.table)?;
        }
    }

    // Columns each CTE must project plainly, and columns each table
    // contributes to the dependency map.
    let mut cte_columns: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut dep_columns: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    dep_columns.entry(root.to_string()).or_default();

    // Step 2: rewrite `{{t}}.col`. Root references become bare qualifiers;
    // related-table references move onto that table's CTE. A reference that
    // names a variable resolves to the variable's CTE projection.
    let mut rewritten = rewrite_table_refs(&formula, |r| {
        let is_variable = variables
            .iter()
            .any(|v| v.table == r.table && v.name == r.column);
        if is_variable {
            return format!("cte_{}.{}", r.table, r.column);
        }

        dep_columns
            .entry(r.table.clone())
            .or_default()
            .insert(r.column.clone());

        if r.table == root {
            format!("{root}.{}", r.column)
        } else {
            cte_columns
                .entry(r.table.clone())
                .or_default()
                .insert(r.column.clone());
            format!("cte_{}.{}", r.table, r.column)
        }
    });

    // Bare variable references resolve the same way.
    for var in &variables {
        let projection = format!("cte_{}.{}", var.table, var.name);
        rewritten = replace_bare_ident(&rewritten, &var.name, &projection);
    }

    // Step 3: one CTE per related table, joined back to the root through the
    // resolved hop chain. Chain prefixes are kept so intermediate tables can
    // build record-locator selectors too.
    let mut cte_tables: BTreeSet<String> = cte_columns.keys().cloned().collect();
    cte_tables.extend(variables.iter().map(|v| v.table.clone()));

    let mut chains: BTreeMap<String, Vec<RelationLink>> = BTreeMap::new();
    let mut ctes: Vec<FormulaCte> = Vec::new();

    for table in &cte_tables {
        let chain = graph.resolve(root, table)?;

        let mut previous = root;
        for (i, link) in chain.iter().enumerate() {
            let (fk_table, fk_column) = hop_columns(previous, &link.table, link.kind);
            dep_columns.entry(fk_table).or_default().insert(fk_column);
            let joined = dep_columns.entry(link.table.clone()).or_default();
            joined.insert(ID_COLUMN.to_string());
            joined.insert(IS_DELETED_COLUMN.to_string());

            chains
                .entry(link.table.clone())
                .or_insert_with(|| chain[..=i].to_vec());
            previous = &link.table;
        }

        ctes.push(build_cte(root, table, &chain, &cte_columns, &variables, &mut dep_columns));
    }

    let sql = assemble(root, column, &rewritten, &ctes);

    // Step 5: dependency entries. The root entry keeps an empty selector --
    // changed root ids are already the target ids.
    let mut dependencies = DependencyMap::new();
    for (table, columns) in &dep_columns {
        let record_ids_selector = if table == root {
            String::new()
        } else {
            let chain = match chains.get(table) {
                Some(chain) => chain.clone(),
                None => graph.resolve(root, table)?,
            };
            build_selector(root, table, &chain)
        };
        dependencies.insert(
            table.clone(),
            ColumnDependency {
                columns: columns.iter().cloned().collect(),
                record_ids_selector,
            },
        );
    }

    Ok(CompiledFormula { sql, dependencies })
}

fn ensure_known_table(models: &ModelsMap, table: &str) -> Result<(), FormulaError> {
    if models.get(table).is_none() {
        return Err(FormulaError::UnknownTable {
            table: table.to_string(),
        });
    }
    Ok(())
}

/// Builds the CTE for one related table: root ids joined through the hop
/// chain, plain columns grouped, variables projected as aggregates.
fn build_cte(
    root: &str,
    table: &str,
    chain: &[RelationLink],
    cte_columns: &BTreeMap<String, BTreeSet<String>>,
    variables: &[Variable],
    dep_columns: &mut BTreeMap<String, BTreeSet<String>>,
) -> FormulaCte {
    let name = format!("{root}_{table}");

    let mut select_list = vec![format!("{root}.id")];
    let mut group_list = vec![format!("{root}.id")];

    if let Some(columns) = cte_columns.get(table) {
        for col in columns {
            select_list.push(format!("{table}.{col}"));
            group_list.push(format!("{table}.{col}"));
        }
    }

    for var in variables.iter().filter(|v| v.table == table) {
        let expr = rewrite_table_refs(&var.expr, |r| {
            dep_columns
                .entry(r.table.clone())
                .or_default()
                .insert(r.column.clone());
            format!("{}.{}", r.table, r.column)
        });
        select_list.push(format!("{expr} AS {}", var.name));
    }

    let joins = if chain.is_empty() {
        String::new()
    } else {
        format!("\n    {}", left_join_chain(root, chain).replace('\n', "\n    "))
    };

    let sql = format!(
        "{name} AS (\n    SELECT {select}\n    FROM {root}\n    JOIN {staging} tdi ON {root}.id = tdi.id{joins}\n    GROUP BY {group}\n)",
        select = select_list.join(", "),
        staging = STAGING_IDS_TABLE,
        group = group_list.join(", "),
    );

    let join = format!("LEFT JOIN {name} cte_{table} ON cte_{table}.id = {root}.id");

    FormulaCte { name, sql, join }
}

/// Inverts a hop chain into the record-locator query for one dependency
/// table: given changed ids of that table, return the root ids to refresh.
fn build_selector(root: &str, table: &str, chain: &[RelationLink]) -> String {
    let joins = inverse_join_chain(root, chain).replace('\n', " ");
    format!(
        "SELECT {root}.id FROM {table} {joins} WHERE {table}.id IN ({{{table}.ids}}) GROUP BY {root}.id"
    )
}

/// Assembles the final statement from the fixed template.
fn assemble(root: &str, column: &str, formula: &str, ctes: &[FormulaCte]) -> String {
    let mut with_block = String::from("WITH ");
    for cte in ctes {
        with_block.push_str(&cte.sql);
        with_block.push_str(",\n");
    }

    let cte_joins = if ctes.is_empty() {
        String::new()
    } else {
        let joins: Vec<&str> = ctes.iter().map(|c| c.join.as_str()).collect();
        format!("\n    {}", joins.join("\n    "))
    };

    format!(
        "{with_block}{root}_{column} AS (\n    SELECT {root}.id, {formula} AS {column}\n    FROM {root}\n    JOIN {staging} tdi ON {root}.id = tdi.id{cte_joins}\n)\nUPDATE {root}\nSET {column} = ct.{column}\nFROM {root}_{column} ct\nWHERE {root}.id = ct.id AND {root}.{column} IS DISTINCT FROM ct.{column}",
        staging = STAGING_IDS_TABLE,
    )
}

#[cfg(test)]
mod tests {
    use cascade_core::model::TableDescriptor;
    use pretty_assertions::assert_eq;

    use super::*;

    fn models() -> ModelsMap {
        ModelsMap::new()
            .register(TableDescriptor::new("company").field("name").field("is_active"))
            .register(
                TableDescriptor::new("contract")
                    .field("company_id")
                    .field("start_date")
                    .field("end_date"),
            )
            .register(
                TableDescriptor::new("invoice")
                    .field("contract_id")
                    .field("total_amount")
                    .field("pending_amount")
                    .field("status"),
            )
            .register(TableDescriptor::new("payment").field("invoice_id").field("amount"))
    }

    fn graph() -> RelationGraph {
        RelationGraph::build(&models())
    }

    #[test]
    fn compile_root_only_formula() {
        let compiled = compile(
            &models(),
            &graph(),
            "invoice",
            "status",
            "CASE WHEN {{invoice}}.pending_amount <= 0 THEN 'Paid' ELSE 'Pending' END",
            "",
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "WITH invoice_status AS (\n\
             \x20   SELECT invoice.id, CASE WHEN invoice.pending_amount <= 0 THEN 'Paid' ELSE 'Pending' END AS status\n\
             \x20   FROM invoice\n\
             \x20   JOIN tmp_dynamiccolumn_ids tdi ON invoice.id = tdi.id\n\
             )\n\
             UPDATE invoice\n\
             SET status = ct.status\n\
             FROM invoice_status ct\n\
             WHERE invoice.id = ct.id AND invoice.status IS DISTINCT FROM ct.status"
        );

        // Root-only formula: one dependency entry, empty selector.
        assert_eq!(compiled.dependencies.len(), 1);
        let root_dep = &compiled.dependencies["invoice"];
        assert_eq!(root_dep.columns, vec!["pending_amount"]);
        assert_eq!(root_dep.record_ids_selector, "");
    }

    #[test]
    fn compile_with_aggregate_variable() {
        let compiled = compile(
            &models(),
            &graph(),
            "invoice",
            "pending_amount",
            "COALESCE({{invoice}}.total_amount - paid_total, {{invoice}}.total_amount)",
            "var paid_total = SUM({{payment}}.amount)",
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "WITH invoice_payment AS (\n\
             \x20   SELECT invoice.id, SUM(payment.amount) AS paid_total\n\
             \x20   FROM invoice\n\
             \x20   JOIN tmp_dynamiccolumn_ids tdi ON invoice.id = tdi.id\n\
             \x20   LEFT JOIN payment ON payment.invoice_id = invoice.id AND payment.is_deleted = false\n\
             \x20   GROUP BY invoice.id\n\
             ),\n\
             invoice_pending_amount AS (\n\
             \x20   SELECT invoice.id, COALESCE(invoice.total_amount - cte_payment.paid_total, invoice.total_amount) AS pending_amount\n\
             \x20   FROM invoice\n\
             \x20   JOIN tmp_dynamiccolumn_ids tdi ON invoice.id = tdi.id\n\
             \x20   LEFT JOIN invoice_payment cte_payment ON cte_payment.id = invoice.id\n\
             )\n\
             UPDATE invoice\n\
             SET pending_amount = ct.pending_amount\n\
             FROM invoice_pending_amount ct\n\
             WHERE invoice.id = ct.id AND invoice.pending_amount IS DISTINCT FROM ct.pending_amount"
        );

        let invoice_dep = &compiled.dependencies["invoice"];
        assert_eq!(invoice_dep.columns, vec!["total_amount"]);
        assert_eq!(invoice_dep.record_ids_selector, "");

        let payment_dep = &compiled.dependencies["payment"];
        assert_eq!(
            payment_dep.columns,
            vec!["amount", "id", "invoice_id", "is_deleted"]
        );
        assert_eq!(
            payment_dep.record_ids_selector,
            "SELECT invoice.id FROM payment JOIN invoice ON payment.invoice_id = invoice.id \
             WHERE payment.id IN ({payment.ids}) GROUP BY invoice.id"
        );
    }

    #[test]
    fn compile_records_intermediate_hops() {
        let compiled = compile(
            &models(),
            &graph(),
            "company",
            "status",
            "CASE WHEN overdue_count > 5 AND {{company}}.is_active = true THEN 'At Risk' ELSE 'Active' END",
            "var overdue_count = COUNT(*) FILTER (WHERE {{invoice}}.status = 'Overdue')",
        )
        .unwrap();

        // contract is an intermediate hop: never referenced, still tracked.
        let contract_dep = &compiled.dependencies["contract"];
        assert_eq!(contract_dep.columns, vec!["company_id", "id", "is_deleted"]);
        assert_eq!(
            contract_dep.record_ids_selector,
            "SELECT company.id FROM contract JOIN company ON contract.company_id = company.id \
             WHERE contract.id IN ({contract.ids}) GROUP BY company.id"
        );

        let invoice_dep = &compiled.dependencies["invoice"];
        assert_eq!(invoice_dep.columns, vec!["contract_id", "id", "is_deleted", "status"]);
        assert_eq!(
            invoice_dep.record_ids_selector,
            "SELECT company.id FROM invoice JOIN contract ON invoice.contract_id = contract.id \
             JOIN company ON contract.company_id = company.id \
             WHERE invoice.id IN ({invoice.ids}) GROUP BY company.id"
        );

        // The full chain appears in the CTE join.
        assert!(compiled.sql.contains(
            "LEFT JOIN contract ON contract.company_id = company.id AND contract.is_deleted = false"
        ));
        assert!(compiled.sql.contains(
            "LEFT JOIN invoice ON invoice.contract_id = contract.id AND invoice.is_deleted = false"
        ));
    }

    #[test]
    fn compile_projects_plain_related_columns() {
        let compiled = compile(
            &models(),
            &graph(),
            "contract",
            "status",
            "CASE WHEN {{company}}.is_active = false THEN 'On Hold' ELSE 'Active' END",
            "",
        )
        .unwrap();

        // Plain (non-aggregate) columns are projected and grouped.
        assert!(compiled.sql.contains(
            "contract_company AS (\n    SELECT contract.id, company.is_active"
        ));
        assert!(compiled.sql.contains("GROUP BY contract.id, company.is_active"));
        assert!(
            compiled.sql.contains("LEFT JOIN contract_company cte_company ON cte_company.id = contract.id")
        );
        assert!(compiled.sql.contains("CASE WHEN cte_company.is_active = false"));
    }

    #[test]
    fn compile_rejects_unknown_table() {
        let err = compile(
            &models(),
            &graph(),
            "invoice",
            "status",
            "{{warehouse}}.stock",
            "",
        )
        .unwrap_err();
        assert_eq!(
            err,
            FormulaError::UnknownTable {
                table: "warehouse".into()
            }
        );
    }

    #[test]
    fn compile_rejects_unreachable_table() {
        let models = ModelsMap::new()
            .register(TableDescriptor::new("invoice").field("total_amount"))
            .register(TableDescriptor::new("employee").field("name"));
        let graph = RelationGraph::build(&models);

        let err = compile(
            &models,
            &graph,
            "invoice",
            "status",
            "{{employee}}.name",
            "",
        )
        .unwrap_err();
        assert!(matches!(err, FormulaError::NoRelation(_)));
    }

    #[test]
    fn compile_rejects_mixed_variable_tables() {
        let err = compile(
            &models(),
            &graph(),
            "invoice",
            "status",
            "x",
            "var x = SUM({{payment}}.amount) + SUM({{contract}}.start_date)",
        )
        .unwrap_err();
        assert!(matches!(err, FormulaError::MixedTablesInVar { .. }));
    }
}
