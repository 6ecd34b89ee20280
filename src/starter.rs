use serde_json::{Value, json};

use crate::domain::CatalogEntry;

pub fn empty_notebook() -> Value {
    notebook(Vec::new())
}

/// Notebook that introduces a downloaded dataset and lists its files.
pub fn starter_notebook(entry: &CatalogEntry, dataset_path: &str) -> Value {
    let quoted = Value::String(dataset_path.to_string()).to_string();
    let mut heading = vec![format!("# {}\n", entry.title)];
    if !entry.subtitle.is_empty() {
        heading.push("\n".to_string());
        heading.push(format!("{}\n", entry.subtitle));
    }
    heading.push("\n".to_string());
    heading.push(format!("Source: [{}]({})", entry.reference, entry.url));

    notebook(vec![
        json!({
            "cell_type": "markdown",
            "metadata": {},
            "source": heading,
        }),
        code_cell(vec![format!("!ls -l -a {dataset_path}")]),
        code_cell(vec![
            "import os\n".to_string(),
            "\n".to_string(),
            format!("dataset_dir = os.path.expanduser({quoted})\n"),
            "for root, _, files in os.walk(dataset_dir):\n".to_string(),
            "    for name in sorted(files):\n".to_string(),
            "        print(os.path.join(root, name))".to_string(),
        ]),
    ])
}

fn code_cell(source: Vec<String>) -> Value {
    json!({
        "cell_type": "code",
        "execution_count": null,
        "metadata": { "trusted": true },
        "outputs": [],
        "source": source,
    })
}

fn notebook(cells: Vec<Value>) -> Value {
    json!({
        "cells": cells,
        "metadata": {
            "kernelspec": {
                "display_name": "Python 3",
                "language": "python",
                "name": "python3",
            },
            "language_info": {
                "codemirror_mode": { "name": "ipython", "version": 3 },
                "file_extension": ".py",
                "mimetype": "text/x-python",
                "name": "python",
                "nbconvert_exporter": "python",
                "pygments_lexer": "ipython3",
            },
        },
        "nbformat": 4,
        "nbformat_minor": 4,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_references_dataset_path() {
        let entry = CatalogEntry::from_ref("ownerA/ds1".parse().unwrap());
        let notebook = starter_notebook(&entry, "~/kaggle/ownerA/ds1");

        assert_eq!(notebook["nbformat"], 4);
        let cells = notebook["cells"].as_array().unwrap();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[1]["source"][0], "!ls -l -a ~/kaggle/ownerA/ds1");
        assert!(cells[2]["source"][2]
            .as_str()
            .unwrap()
            .contains("\"~/kaggle/ownerA/ds1\""));
    }
}
