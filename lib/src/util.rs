use crate::errors::{OrmError, Result};

use std::io::{BufReader, Write};
use std::path::Path;

use oxigraph::io::{RdfFormat, RdfParser, RdfSerializer};
use oxigraph::model::{Graph, Triple};

use log::{debug, info};

/// Guesses the serialization from the file extension, defaulting to Turtle.
pub fn format_for(path: &Path) -> RdfFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("xml") | Some("rdf") | Some("owl") => RdfFormat::RdfXml,
        Some("nt") => RdfFormat::NTriples,
        Some("nq") => RdfFormat::NQuads,
        Some("trig") => RdfFormat::TriG,
        _ => RdfFormat::Turtle,
    }
}

/// Reads every statement of an RDF file into one graph. Graph names in
/// quad formats are dropped.
pub fn read_file(path: &Path) -> Result<Graph> {
    debug!("Reading file: {}", path.display());
    let file = std::fs::File::open(path)?;
    let parser = RdfParser::from_format(format_for(path)).for_reader(BufReader::new(file));
    let mut graph = Graph::new();
    for quad in parser {
        let quad = quad.map_err(|e| {
            OrmError::data_source(format!("cannot parse {}: {}", path.display(), e))
        })?;
        graph.insert(&Triple::new(quad.subject, quad.predicate, quad.object));
    }
    Ok(graph)
}

/// Writes a graph as N-Triples.
pub fn write_ntriples<W: Write>(graph: &Graph, writer: W) -> Result<W> {
    let mut serializer = RdfSerializer::from_format(RdfFormat::NTriples).for_writer(writer);
    for triple in graph.iter() {
        serializer.serialize_triple(triple)?;
    }
    Ok(serializer.finish()?)
}

/// Writes a graph to a file, choosing the format from its extension.
pub fn write_file(graph: &Graph, path: &Path) -> Result<()> {
    info!(
        "Writing {} statements to {}",
        graph.len(),
        path.display()
    );
    let file = std::fs::File::create(path)?;
    let mut serializer = RdfSerializer::from_format(format_for(path)).for_writer(file);
    for triple in graph.iter() {
        serializer.serialize_triple(triple)?;
    }
    serializer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxigraph::model::{Literal, NamedNode};

    fn sample() -> Graph {
        let mut g = Graph::new();
        g.insert(&Triple::new(
            NamedNode::new("http://example.org/a").unwrap(),
            NamedNode::new("http://example.org/name").unwrap(),
            Literal::new_simple_literal("A"),
        ));
        g
    }

    #[test]
    fn test_read_file() {
        let dir = tempfile::tempdir().unwrap();
        let ttl = dir.path().join("model.ttl");
        std::fs::write(
            &ttl,
            "@prefix ex: <http://example.org/> .\nex:a ex:name \"A\" ; ex:age 3 .\n",
        )
        .unwrap();
        assert_eq!(read_file(&ttl).unwrap().len(), 2);

        let nt = dir.path().join("model.nt");
        write_file(&sample(), &nt).unwrap();
        assert_eq!(read_file(&nt).unwrap(), sample());

        assert!(read_file(&dir.path().join("missing.ttl")).is_err());

        let broken = dir.path().join("broken.ttl");
        std::fs::write(&broken, "this is not turtle").unwrap();
        let err = read_file(&broken).unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::DataSourceFault);
    }

    #[test]
    fn test_write_ntriples() {
        let out = write_ntriples(&sample(), Vec::new()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text.trim(),
            "<http://example.org/a> <http://example.org/name> \"A\" ."
        );
    }
}
