//! Job descriptor files: one job per line, `input_file[,command line]`.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// 1-based line in the descriptor file.
    pub line: usize,
    pub input_file: String,
    pub command_line: Option<String>,
}

/// Parse one descriptor line. Blank lines carry no job.
///
/// Everything after the first comma is the command line, so arguments may
/// themselves contain commas.
pub fn parse_line(line_no: usize, line: &str) -> Option<JobDescriptor> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (file, cmd) = match line.split_once(',') {
        Some((f, c)) => (f.trim(), Some(c.trim())),
        None => (line, None),
    };
    Some(JobDescriptor {
        line: line_no,
        input_file: file.to_string(),
        command_line: cmd.filter(|c| !c.is_empty()).map(str::to_string),
    })
}

pub fn parse(text: &str) -> Vec<JobDescriptor> {
    text.lines()
        .enumerate()
        .filter_map(|(i, l)| parse_line(i + 1, l))
        .collect()
}

/// Distinct input files, sorted.
pub fn unique_inputs(jobs: &[JobDescriptor]) -> BTreeSet<String> {
    jobs.iter().map(|j| j.input_file.clone()).collect()
}

/// Physical name of a batch input file in the download tree.
pub fn staged_name(batch_id: i64, name: &str) -> String {
    format!("bf_{}_{}", batch_id, name)
}

/// One `create_work --stdin` line.
pub fn submission_line(batch_id: i64, job: &JobDescriptor) -> String {
    let staged = staged_name(batch_id, &job.input_file);
    match &job.command_line {
        Some(cmd) => format!("--command_line \"{}\" {}", cmd, staged),
        None => staged,
    }
}

/// Full stdin payload for `create_work`, newline-terminated.
pub fn submission_payload(batch_id: i64, jobs: &[JobDescriptor]) -> String {
    let mut out = String::new();
    for job in jobs {
        out.push_str(&submission_line(batch_id, job));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "input0.json,--arg=5 --verbose\n\
                          \n  input1.json , --arg=4  \n\
                          input0.json\n\
                          input2.json,\n\
                          input3.json,--pair=1,2\n";

    #[test]
    fn parses_lines_and_skips_blanks() {
        let jobs = parse(SAMPLE);
        assert_eq!(jobs.len(), 5);
        assert_eq!(jobs[0].input_file, "input0.json");
        assert_eq!(jobs[0].command_line.as_deref(), Some("--arg=5 --verbose"));
        assert_eq!(jobs[1].line, 3);
        assert_eq!(jobs[1].input_file, "input1.json");
        assert_eq!(jobs[1].command_line.as_deref(), Some("--arg=4"));
        assert_eq!(jobs[2].command_line, None);
        assert_eq!(jobs[3].command_line, None);
        assert_eq!(jobs[4].command_line.as_deref(), Some("--pair=1,2"));
    }

    #[test]
    fn unique_inputs_collapse_duplicates() {
        let jobs = parse(SAMPLE);
        let uniq: Vec<String> = unique_inputs(&jobs).into_iter().collect();
        assert_eq!(
            uniq,
            vec!["input0.json", "input1.json", "input2.json", "input3.json"]
        );
        assert!(uniq.len() <= jobs.len());
    }

    #[test]
    fn payload_lines() {
        let jobs = parse("a.json,--x 1\nb.json\n");
        assert_eq!(
            submission_payload(12, &jobs),
            "--command_line \"--x 1\" bf_12_a.json\nbf_12_b.json\n"
        );
        assert_eq!(staged_name(3, "in.json"), "bf_3_in.json");
    }
}
