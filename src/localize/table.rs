//! Canonical author names and their Korean display forms.
//!
//! Keys are the names as they appear in library filenames and quoted
//! passages; a few carry the year span the source texts print alongside
//! them. Order here is cosmetic: matching sorts entries by name length
//! at load so longer forms ("Augustine of Hippo") always win first.

pub(crate) const AUTHORS: &[(&str, &str)] = &[
    ("Herman Bavinck (1854-1921)", "헤르만 바빙크"),
    ("John Calvin (1509-1564)", "장 칼뱅"),
    ("Martin Luther (1483-1546)", "마르틴 루터"),
    ("Jonathan Edwards (1703-1758)", "조나단 에드워즈"),
    ("Augustine of Hippo", "히포의 아우구스티누스"),
    ("Augustine", "아우구스티누스"),
    ("Thomas Aquinas", "토마스 아퀴나스"),
    ("Anselm of Canterbury", "캔터베리의 안셀무스"),
    ("Athanasius", "아타나시우스"),
    ("John Chrysostom", "요하네스 크리소스토무스"),
    ("John Owen", "존 오웬"),
    ("John Bunyan", "존 번연"),
    ("Richard Baxter", "리처드 백스터"),
    ("Thomas Watson", "토마스 왓슨"),
    ("Thomas Boston", "토마스 보스턴"),
    ("John Flavel", "존 플라벨"),
    ("Stephen Charnock", "스티븐 차녹"),
    ("William Perkins", "윌리엄 퍼킨스"),
    ("Samuel Rutherford", "사무엘 러더퍼드"),
    ("Wilhelmus à Brakel", "빌헬무스 아 브라켈"),
    ("Petrus van Mastricht", "페트루스 판 마스트리흐트"),
    ("Francis Turretin", "프란시스 튜레틴"),
    ("Zacharias Ursinus", "자카리아스 우르시누스"),
    ("Heinrich Bullinger", "하인리히 불링거"),
    ("Ulrich Zwingli", "울리히 츠빙글리"),
    ("John Knox", "존 녹스"),
    ("John Wesley", "존 웨슬리"),
    ("George Whitefield", "조지 휫필드"),
    ("Matthew Henry", "매튜 헨리"),
    ("Charles Spurgeon", "찰스 스펄전"),
    ("Charles Hodge", "찰스 하지"),
    ("A. A. Hodge", "A. A. 하지"),
    ("B. B. Warfield", "B. B. 워필드"),
    ("Abraham Kuyper", "아브라함 카이퍼"),
    ("Louis Berkhof", "루이스 벌코프"),
    ("Geerhardus Vos", "게르할더스 보스"),
    ("Cornelius Van Til", "코르넬리우스 반틸"),
    ("J. Gresham Machen", "그레샴 메이첸"),
    ("John Murray", "존 머리"),
    ("John Gill", "존 길"),
];
