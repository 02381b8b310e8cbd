//! Human-readable assignment report.

use classgrid_core::Roster;
use classgrid_pipeline::RepairRecord;
use classgrid_scoring::ScoredScenario;

pub fn format_report(
    roster: &Roster,
    best: &ScoredScenario,
    repair: Option<&RepairRecord>,
) -> String {
    let scenario = &best.scenario;
    let b = &best.breakdown;
    let mut out = String::new();

    out.push_str("\n╔══════════════════════════════════════════╗\n");
    out.push_str("║  classgrid assignment                    ║\n");
    out.push_str("╠══════════════════════════════════════════╣\n");
    out.push_str(&format!("║  Scenario: {:<30}║\n", scenario.id()));
    out.push_str(&format!("║  Roster:   {:<30}║\n", format!("{} individuals", roster.len())));
    out.push_str(&format!("║  Penalty:  {:<30}║\n", b.total));
    out.push_str("╚══════════════════════════════════════════╝\n\n");

    out.push_str(&format!(
        "Penalties: population {}, gender {}, language {}, performance {}, conflicts {}, \
         broken {}\n",
        b.population_penalty,
        b.gender_penalty,
        b.language_penalty,
        b.performance_penalty,
        b.conflict_penalty,
        b.broken_penalty,
    ));
    out.push_str(&format!(
        "Differences: population {}, boys {}, girls {}, language {}; tier spreads {:?}\n",
        b.diff_population, b.diff_boys, b.diff_girls, b.diff_language, b.performance_spreads,
    ));
    if let Some(repair) = repair {
        let tier = &repair.tier;
        out.push_str(&format!(
            "Repair: {} balance swaps; performance tier {} {} (spreads {} / {})\n",
            repair.balance_swaps.len(),
            tier.tier,
            if tier.met { "met" } else { "not met" },
            tier.spread_one,
            tier.spread_three,
        ));
    }
    out.push('\n');

    out.push_str("Group  Total  Boys  Girls  Lang  F  HE  SN  T1  T2  T3\n");
    for g in &b.groups {
        out.push_str(&format!(
            "{:<5}  {:>5}  {:>4}  {:>5}  {:>4}  {}  {:>2}  {:>2}  {:>2}  {:>2}  {:>2}\n",
            g.label,
            g.total,
            g.boys,
            g.girls,
            g.good_language,
            g.founders,
            g.high_energy,
            g.special_needs,
            g.performance[0],
            g.performance[1],
            g.performance[2],
        ));
    }
    out.push('\n');

    for (group, g) in b.groups.iter().enumerate() {
        let names: Vec<&str> = scenario
            .members(group)
            .into_iter()
            .map(|id| roster.name(id))
            .collect();
        out.push_str(&format!("{}: {}\n", g.label, names.join(", ")));
    }
    out.push('\n');

    if !b.unresolved_incompatibilities.is_empty() {
        out.push_str("UNRESOLVED CONFLICTS:\n");
        for c in &b.unresolved_incompatibilities {
            out.push_str(&format!("  • {} / {} in {}\n", c.first, c.second, c.group));
        }
        out.push('\n');
    }

    if !b.broken_pairs.is_empty() {
        out.push_str("SEPARATED PAIRS:\n");
        for p in &b.broken_pairs {
            out.push_str(&format!(
                "  • {} ({}) / {} ({})\n",
                p.first, p.first_group, p.second, p.second_group
            ));
        }
        out.push('\n');
    }

    if !scenario.notes().is_empty() {
        out.push_str("NOTES:\n");
        for note in scenario.notes() {
            out.push_str(&format!("  • {}: {}\n", note.phase, note.message));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use classgrid_core::{
        EngineConfig, Gender, Phase, PhaseContext, Relations, RosterRecord, Scenario,
    };
    use classgrid_pipeline::Pipeline;
    use classgrid_scoring::rank_scenarios;

    fn person(name: &str, gender: Gender, friends: &[&str], conflicts: &[&str]) -> RosterRecord {
        RosterRecord {
            name: name.to_string(),
            gender,
            good_language: true,
            flags: Default::default(),
            performance: Default::default(),
            friends: friends.iter().map(|s| s.to_string()).collect(),
            conflicts: conflicts.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn report_lists_groups_and_members() {
        let records = vec![
            person("Ada", Gender::Girl, &[], &[]),
            person("Ben", Gender::Boy, &[], &[]),
            person("Cy", Gender::Boy, &[], &[]),
            person("Di", Gender::Girl, &[], &[]),
        ];
        let outcome = Pipeline::default().run(records).unwrap();
        let best = outcome.selected().unwrap();
        let text = format_report(&outcome.roster, best, outcome.repair_of(best.scenario.id()));

        assert!(text.contains("classgrid assignment"));
        assert!(text.contains("4 individuals"));
        assert!(text.contains("A1: "));
        assert!(text.contains("A2: "));
        for name in ["Ada", "Ben", "Cy", "Di"] {
            assert!(text.contains(name), "{name} missing");
        }
        assert!(!text.contains("UNRESOLVED CONFLICTS"));
        assert!(text.contains("performance tier T"));
    }

    #[test]
    fn anomalies_are_listed() {
        let records = vec![
            person("Ada", Gender::Girl, &["Ben"], &[]),
            person("Ben", Gender::Boy, &["Ada"], &[]),
            person("Cy", Gender::Boy, &[], &["Di"]),
            person("Di", Gender::Girl, &[], &[]),
        ];
        let roster = Roster::from_records(records, Some(2), 25).unwrap();
        let relations = Relations::build(&roster);
        let config = EngineConfig::default();
        let ctx = PhaseContext::new(&roster, &relations, &config);

        let mut scenario = Scenario::root(&roster);
        for (id, group) in [(0, 0), (1, 1), (2, 0), (3, 0)] {
            scenario.place(roster.get(id), group, Phase::Residual).unwrap();
        }
        let ranked = rank_scenarios(&ctx, vec![scenario]);
        let text = format_report(&roster, &ranked[0], None);

        assert!(text.contains("UNRESOLVED CONFLICTS:\n  • Cy / Di in A1"));
        assert!(text.contains("SEPARATED PAIRS:\n  • Ada (A1) / Ben (A2)"));
    }
}
