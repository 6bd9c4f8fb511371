use crate::graph::{post_order, Node, NodeRef};
use crate::nameenv::NameEnv;
use crate::utils::join_into_string;

use prettytable::{self, format, row};

use std::io;
use std::sync::Arc;

/// Prints the graphs ending at `roots` to stdout, one node per row.
pub fn pprint(roots: &[NodeRef]) {
    build_table(roots).printstd();
}

pub fn pprint_write<W: io::Write + ?Sized>(roots: &[NodeRef], out: &mut W) -> io::Result<()> {
    build_table(roots).print(out)?;
    Ok(())
}

pub fn pprint_string(roots: &[NodeRef]) -> String {
    build_table(roots).to_string()
}

fn build_table(roots: &[NodeRef]) -> prettytable::Table {
    let nodes = post_order(roots);
    let mut name_env: NameEnv<'_, Node> = NameEnv::new();

    let mut table = prettytable::Table::new();
    table.set_titles(row!["Node", "Op", "Operands", "Shape", "Scope"]);
    for node in &nodes {
        // Operands precede users, so their names already exist.
        let operands = join_into_string(
            node.operands()
                .iter()
                .map(|o| name_env.get_name_or_display(o)),
            ", ",
        );
        let name = name_env.name(&**node).to_owned();
        let scope = node.metadata().scope.as_deref().unwrap_or("");
        table.add_row(row![name, node.op(), operands, node.shape(), scope]);
    }

    // Roots which aren't last are easy to miss.
    if roots.len() > 1 || roots.last().map(Arc::as_ptr) != nodes.last().map(Arc::as_ptr) {
        let names = join_into_string(roots.iter().map(|r| name_env.get_name_or_display(r)), ", ");
        table.add_row(row!["", format!("return {names}"), "", "", ""]);
    }

    let format = format::FormatBuilder::new()
        .separator(
            format::LinePosition::Title,
            format::LineSeparator::new('-', ' ', ' ', ' '),
        )
        .column_separator(' ')
        .build();
    table.set_format(format);
    table
}
