// Rebuild report.csv / report.html from a saved report.json
use colored::*;
use osintrust::report_generator::{load_report, write_reports, ReportFormat};
use std::path::{Path, PathBuf};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: regen_report <scan_directory | report.json>");
        eprintln!("Example: regen_report osint_results/example.com");
        std::process::exit(1);
    }

    let input = Path::new(&args[1]);
    let (report_path, out_dir): (PathBuf, PathBuf) = if input.is_dir() {
        (input.join("report.json"), input.to_path_buf())
    } else {
        let parent = input.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."));
        (input.to_path_buf(), parent)
    };

    if !report_path.exists() {
        eprintln!("{}", format!("[ERROR] Report not found: {}", report_path.display()).red());
        std::process::exit(1);
    }

    let report = match load_report(&report_path) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{}", format!("[ERROR] {:#}", e).red());
            std::process::exit(1);
        }
    };

    println!("{}", format!("[*] Regenerating reports for: {}", report.domain).cyan());

    match write_reports(&report, &out_dir, &[ReportFormat::Csv, ReportFormat::Html]) {
        Ok(paths) => {
            for path in paths {
                println!("{}", format!("[+] Written: {}", path.display()).green());
            }
        }
        Err(e) => {
            eprintln!("{}", format!("[ERROR] Failed to write reports: {:#}", e).red());
            std::process::exit(1);
        }
    }
}
