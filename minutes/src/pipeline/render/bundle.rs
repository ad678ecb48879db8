//! Inline style and script shared by both renderers.

pub const STYLE: &str = r#"<style>
:root { --ink: #1f2933; --muted: #616e7c; --accent: #1d4ed8; --line: #d9e2ec; --soft: #f5f7fa; }
* { box-sizing: border-box; }
body { margin: 0; font-family: "Sarabun", "Segoe UI", Arial, sans-serif; color: var(--ink); background: #fff; line-height: 1.6; }
main { max-width: 960px; margin: 0 auto; padding: 24px 32px 64px; }
h1, h2, h3 { line-height: 1.3; }
h2 { border-bottom: 2px solid var(--accent); padding-bottom: 4px; margin-top: 40px; }
.cover { text-align: center; padding: 48px 0 32px; border-bottom: 1px solid var(--line); }
.cover .label { letter-spacing: .2em; text-transform: uppercase; color: var(--muted); font-size: 13px; }
.cover h1 { font-size: 30px; margin: 12px 0; }
.meta-grid { display: grid; grid-template-columns: max-content 1fr; gap: 4px 16px; text-align: left; max-width: 560px; margin: 16px auto 0; }
.meta-grid dt { color: var(--muted); }
.meta-grid dd { margin: 0; }
table { border-collapse: collapse; width: 100%; margin: 12px 0; font-size: 14px; }
th, td { border: 1px solid var(--line); padding: 6px 8px; vertical-align: top; text-align: left; }
th { background: var(--soft); }
.stats { display: flex; gap: 12px; flex-wrap: wrap; margin: 16px 0; }
.stat { flex: 1 1 140px; background: var(--soft); border-radius: 8px; padding: 12px; text-align: center; }
.stat b { display: block; font-size: 24px; color: var(--accent); }
.topic { border: 1px solid var(--line); border-radius: 8px; padding: 16px 20px; margin: 20px 0; page-break-inside: avoid; }
.topic-meta { color: var(--muted); font-size: 14px; }
.resolution { background: #eef6ee; border-left: 4px solid #2f855a; padding: 8px 12px; margin: 12px 0; }
.figure { margin: 12px 0; text-align: center; }
.figure img { max-width: 100%; border: 1px solid var(--line); border-radius: 4px; cursor: zoom-in; }
.figure figcaption, .doc-ref { color: var(--muted); font-size: 13px; }
.pair { display: flex; gap: 12px; }
.pair figure { flex: 1; margin: 0; }
.filter-bar { position: sticky; top: 0; background: #fff; padding: 8px 0; display: flex; gap: 8px; flex-wrap: wrap; border-bottom: 1px solid var(--line); z-index: 5; }
.filter-bar button { border: 1px solid var(--accent); background: #fff; color: var(--accent); border-radius: 16px; padding: 4px 12px; cursor: pointer; }
.filter-bar button.active { background: var(--accent); color: #fff; }
.timeline-bar { position: relative; height: 28px; background: var(--soft); border-radius: 4px; margin: 12px 0; }
.timeline-bar span { position: absolute; top: 0; bottom: 0; background: var(--accent); opacity: .75; border-right: 1px solid #fff; }
.lb-overlay { display: none; position: fixed; inset: 0; background: rgba(0,0,0,.85); align-items: center; justify-content: center; z-index: 50; }
.lb-overlay.open { display: flex; }
.lb-overlay img { max-width: 92vw; max-height: 92vh; }
@media print { .filter-bar, .lb-overlay { display: none !important; } main { padding: 0; } @page { size: A4; margin: 16mm; } }
</style>"#;

pub const SCRIPT: &str = r#"<script>
document.addEventListener('DOMContentLoaded', function () {
  if (!document.getElementById('lb-overlay')) {
    document.body.insertAdjacentHTML('beforeend', '<div id="lb-overlay" class="lb-overlay"><img id="lb-img" alt=""></div>');
  }
  var overlay = document.getElementById('lb-overlay');
  var target = document.getElementById('lb-img');
  document.querySelectorAll('img[data-lightbox]').forEach(function (img) {
    img.addEventListener('click', function () { target.src = img.src; overlay.classList.add('open'); });
  });
  overlay.addEventListener('click', function () { overlay.classList.remove('open'); });
  document.addEventListener('keydown', function (e) { if (e.key === 'Escape') { overlay.classList.remove('open'); } });
  document.querySelectorAll('.filter-bar button').forEach(function (btn) {
    btn.addEventListener('click', function () {
      document.querySelectorAll('.filter-bar button').forEach(function (b) { b.classList.remove('active'); });
      btn.classList.add('active');
      var dept = btn.getAttribute('data-dept');
      document.querySelectorAll('.topic').forEach(function (t) {
        t.style.display = (!dept || t.getAttribute('data-dept') === dept) ? '' : 'none';
      });
    });
  });
});
</script>"#;

/// Style followed by script, as placed inside `<head>`.
pub fn head_bundle() -> String {
    format!("{STYLE}\n{SCRIPT}")
}
