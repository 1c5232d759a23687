/// Stats and triage lists from one extraction run. Nothing is ever dropped
/// without a trace: every entity lands in exactly one of the triage lists
/// or in the unchanged count.
#[derive(Debug, Default)]
pub struct RunReport {
    pub manuscripts_processed: u32,
    pub manuscripts_unchanged: u32,
    pub manuscripts_failed: u32,
    pub fragments_classified: u32,
    pub fragments_unparsed: u32,
    pub assignments_created: u32,
    pub assignments_updated: u32,
    pub merge_conflicts: u32,
    pub changes_recorded: u32,
    pub overdue_transitions: u32,
    pub emails_matched: u32,
    pub email_disagreements: u32,
    pub concurrency_conflicts: u32,

    /// Entity ids updated with no conflict and no unparsed fragments.
    pub confidently_updated: Vec<String>,
    /// Entity ids carrying a merge conflict or an email disagreement.
    pub flagged_for_review: Vec<String>,
    /// Raw fragment text that matched no grammar variant, kept for audit.
    pub unparsed: Vec<String>,
}

impl RunReport {
    pub fn flag(&mut self, entity_id: &str) {
        if !self.flagged_for_review.iter().any(|e| e == entity_id) {
            self.flagged_for_review.push(entity_id.to_string());
        }
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Extraction Run Complete ===")?;
        writeln!(f, "Manuscripts processed: {}", self.manuscripts_processed)?;
        writeln!(f, "Manuscripts unchanged: {}", self.manuscripts_unchanged)?;
        writeln!(f, "Manuscripts failed:    {}", self.manuscripts_failed)?;
        writeln!(f, "Fragments classified:  {}", self.fragments_classified)?;
        writeln!(f, "Fragments unparsed:    {}", self.fragments_unparsed)?;
        writeln!(f, "Assignments created:   {}", self.assignments_created)?;
        writeln!(f, "Assignments updated:   {}", self.assignments_updated)?;
        writeln!(f, "Merge conflicts:       {}", self.merge_conflicts)?;
        writeln!(f, "Changes recorded:      {}", self.changes_recorded)?;
        writeln!(f, "Overdue transitions:   {}", self.overdue_transitions)?;
        writeln!(f, "Emails matched:        {}", self.emails_matched)?;
        writeln!(f, "Email disagreements:   {}", self.email_disagreements)?;
        writeln!(f, "Concurrency conflicts: {}", self.concurrency_conflicts)?;
        writeln!(f, "\nTriage:")?;
        writeln!(f, "  Confidently updated: {}", self.confidently_updated.len())?;
        writeln!(f, "  Flagged for review:  {}", self.flagged_for_review.len())?;
        writeln!(f, "  Unparsed inputs:     {}", self.unparsed.len())?;
        Ok(())
    }
}
