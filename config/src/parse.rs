use crate::Error;

/// Parse the text of one layer file into `((section, key), value)` entries,
/// in file order.
///
/// Format is one option per line: `section.key = value`. The section/key
/// split is the last `.` on the left-hand side, so sections themselves may
/// be dotted (`step.mesh.command` is key `command` in section `step.mesh`).
/// Blank lines and lines starting with `#` are ignored.
pub fn parse_layer(layer_name: &str, text: &str) -> Result<Vec<((String, String), String)>, Error> {
    let mut options = Vec::with_capacity(32);

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (lhs, value) = line.split_once('=').ok_or_else(|| parse_err(layer_name, lineno, raw))?;
        let (section, key) = lhs
            .trim()
            .rsplit_once('.')
            .ok_or_else(|| parse_err(layer_name, lineno, raw))?;

        if section.is_empty() || key.is_empty() {
            return Err(parse_err(layer_name, lineno, raw));
        }

        options.push((
            (section.to_owned(), key.to_owned()),
            value.trim().to_owned(),
        ));
    }

    Ok(options)
}

fn parse_err(layer: &str, lineno: usize, text: &str) -> Error {
    Error::Parse {
        layer: layer.to_owned(),
        line: lineno + 1,
        text: text.trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let opts = parse_layer(
            "base",
            "# comment\n\
             run.work-dir = /tmp/work\n\
             \n\
             step.mesh.command = genmesh --out mesh.dat\n",
        )
        .unwrap();

        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].0, ("run".to_owned(), "work-dir".to_owned()));
        assert_eq!(opts[0].1, "/tmp/work");
        assert_eq!(opts[1].0, ("step.mesh".to_owned(), "command".to_owned()));
        assert_eq!(opts[1].1, "genmesh --out mesh.dat");
    }

    #[test]
    fn test_parse_value_may_contain_equals() {
        let opts = parse_layer("base", "step.solve.command = solver --eps=1e-9\n").unwrap();
        assert_eq!(opts[0].1, "solver --eps=1e-9");
    }

    #[test]
    fn test_parse_rejects_undotted_lhs() {
        let err = parse_layer("base", "workdir = /tmp\n").unwrap_err();
        match err {
            Error::Parse { layer, line, .. } => {
                assert_eq!(layer, "base");
                assert_eq!(line, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_rejects_missing_equals() {
        assert!(parse_layer("base", "run.work-dir /tmp\n").is_err());
    }
}
