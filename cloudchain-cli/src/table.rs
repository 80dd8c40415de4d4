use std::io::IsTerminal;

use comfy_table::{Attribute, Cell, Table, presets::NOTHING};

/// Output styling for tables, decided once per invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CliTableTheme {
    pub use_color: bool,
}

impl CliTableTheme {
    pub(crate) fn detect() -> Self {
        let is_tty = std::io::stdout().is_terminal();
        let no_color = std::env::var_os("NO_COLOR").is_some();
        theme_for(is_tty, no_color)
    }

    pub(crate) fn data_table(self, headers: &[&str]) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_header(headers.iter().map(|h| self.bold(h)).collect::<Vec<_>>());
        table
    }

    pub(crate) fn kv_table(self) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table
    }

    pub(crate) fn kv_row(self, table: &mut Table, key: &str, value: impl ToString) {
        table.add_row(vec![self.bold(key), Cell::new(value.to_string())]);
    }

    fn bold(self, text: &str) -> Cell {
        let cell = Cell::new(text);
        if self.use_color {
            cell.add_attribute(Attribute::Bold)
        } else {
            cell
        }
    }
}

fn theme_for(is_tty: bool, no_color: bool) -> CliTableTheme {
    CliTableTheme {
        use_color: is_tty && !no_color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_only_on_a_terminal() {
        assert!(theme_for(true, false).use_color);
        assert!(!theme_for(false, false).use_color);
    }

    #[test]
    fn no_color_wins() {
        assert!(!theme_for(true, true).use_color);
    }

    #[test]
    fn data_table_has_no_borders() {
        let theme = theme_for(false, true);
        let mut table = theme.data_table(&["NAME", "SIZE"]);
        table.add_row(vec!["a.bin", "3 B"]);
        let rendered = table.to_string();
        assert!(rendered.contains("NAME"));
        assert!(rendered.contains("a.bin"));
        assert!(!rendered.contains('|'));
        assert!(!rendered.contains('+'));
    }

    #[test]
    fn kv_rows_render_key_and_value() {
        let theme = theme_for(false, true);
        let mut table = theme.kv_table();
        theme.kv_row(&mut table, "Active", 3);
        let rendered = table.to_string();
        assert!(rendered.contains("Active"));
        assert!(rendered.contains('3'));
    }
}
