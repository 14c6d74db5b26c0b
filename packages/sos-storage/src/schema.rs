pub fn render_schema() -> &'static str {
	include_str!("../../../sql/init.sql")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn table_columns(table: &str) -> Vec<String> {
		let schema = render_schema();
		let header = format!("CREATE TABLE IF NOT EXISTS {table} (");
		let start = schema.find(&header).expect("Table should be declared.") + header.len();
		let body = &schema[start..];
		let end = body.find(");").expect("Table should be closed.");

		body[..end]
			.lines()
			.filter_map(|line| line.split_whitespace().next())
			.map(str::to_string)
			.collect()
	}

	#[test]
	fn taxa_table_only_holds_relations() {
		assert_eq!(table_columns("taxa"), ["taxon_id", "parent_id", "secondary_parent_ids"]);
	}
}
